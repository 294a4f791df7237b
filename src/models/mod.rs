pub mod result_record;
pub mod status;
pub mod work_item;

pub use result_record::*;
pub use status::*;
pub use work_item::*;
