pub mod secret_provisioner;
pub mod sequence_counter;
pub mod user_service;
pub mod workspace;

pub use secret_provisioner::SecretProvisioner;
pub use sequence_counter::SequenceCounter;
pub use user_service::{NewUser, UserError, UserRecord, UserService, UserUpdate, UserView};
pub use workspace::{WorkspaceError, WorkspaceProvisioner};
