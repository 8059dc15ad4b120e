//! Typed values and their pooled lifetime management for the Sylva transformation
//! runtime, together with the node model every document representation implements.
pub mod error;
pub mod fragment;
pub mod guard;
pub mod model;
pub mod node_list;
pub mod pool;
pub mod value;

pub use error::{Error, ErrorCode};
pub use fragment::FragmentNode;
pub use guard::OwnershipGuard;
pub use model::{NodeKind, QName, XdmNode};
pub use node_list::{MutableNodeList, NodeList};
pub use pool::{PoolId, PoolStats, ValueHandle, ValuePool};
pub use value::{ResultTreeFragment, Span, TypedValue, ValueKind, ValuePayload};
