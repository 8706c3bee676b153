// Handler panic isolation
use std::any::Any;
use tokio::task::JoinError;

/// Turn a failed handler task into the message recorded as `lastError`
pub(crate) fn describe_join_error(err: JoinError) -> String {
    if err.is_panic() {
        format!("handler panicked: {}", panic_message(err.into_panic()))
    } else {
        format!("handler cancelled: {err}")
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
