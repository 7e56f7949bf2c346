pub mod alter;
pub mod descriptor;
pub mod options;
pub mod redact;
pub mod sink;
pub mod statement;
pub mod targets;
pub mod view;

pub use alter::{AlterChangefeed, AlterationDelta};
pub use descriptor::ChangefeedDescriptor;
pub use options::{Format, OptionBag};
pub use sink::{SinkAddress, SinkKind};
pub use targets::TargetSet;
pub use view::{IntrospectionRow, JobSnapshot, RowOrder, SortKey};
