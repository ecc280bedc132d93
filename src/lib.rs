pub mod base;
pub mod context;
pub mod errors;
pub mod hooks;
pub mod models;
pub mod options;
pub mod query;
pub mod registry;
pub mod response;
pub mod router;
pub mod routes;
pub mod storage;
pub mod traits;

pub use base::BasicModel;
pub use context::{RequestContext, deadline_middleware};
pub use errors::ApiError;
pub use models::RequestOptions;
pub use options::{CreateOption, CrudOption, DeleteOption, GetOption, ListOption, Operation, UpdateOption};
pub use query::QueryTransformation;
pub use registry::{Registry, RegistryError};
pub use response::Envelope;
pub use router::{crud, crud_nested, id_param};
pub use storage::{MemoryStorage, SeaOrmStorage, Storage, StorageError};
pub use traits::{Identity, Model};
