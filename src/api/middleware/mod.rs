pub mod admin_auth;
pub mod trace_id;

pub use admin_auth::AdminAuth;
pub use trace_id::{trace_id_middleware, TraceId};
