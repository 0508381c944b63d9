pub mod authz;
pub mod challenge;
pub mod context;
pub mod flow;
pub(crate) mod http01;
pub(crate) mod tls_alpn01;
pub(crate) mod tls_sni01;
pub mod types;

pub use authz::Authorization;
pub use challenge::{ChallengeKind, respond, select_challenge};
pub use context::{AcmeContext, AcmeResponse};
pub use flow::{authorize_domain, deactivate_authorization};
pub use types::{AuthzState, Challenge};
