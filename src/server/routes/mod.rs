mod gateway;

pub use gateway::*;

#[derive(serde::Serialize)]
pub struct ErrorResponse {
    message: &'static str,
}
