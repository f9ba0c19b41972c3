pub mod subjects;
mod transport;

pub use subjects::{sanitize_subject_token, subject_for};
pub use transport::NatsTransport;
