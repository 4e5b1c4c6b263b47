use std::fmt;

/// Logs a failed task the way every task in the daemon does.
pub fn log_failure<E>(context: &str, result: Result<(), E>)
where
    E: fmt::Display + fmt::Debug,
{
    if let Err(e) = result {
        log::error!("{}: {}", context, e);
        log::debug!("Details: {:?}", e)
    }
}
