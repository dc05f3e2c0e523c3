mod labels;
mod mbox;
mod normalize;
mod thread;
mod threading;
mod types;

pub use labels::{Classified, LabelClassifier};
pub use mbox::{MailSource, MboxSource, is_mbox};
pub use normalize::{Normalizer, extract_address};
pub use thread::{Thread, ThreadRules};
pub use threading::{Folded, ThreadBook};
pub use types::{MailDate, Message, RawMessage};
