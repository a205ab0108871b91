//! This module provides a built-in logger implementation.
//!
//! The built-in logger implementation uses the `env_logger` crate. It is
//! enabled by the Cargo feature "builtin_env_logger", which is enabled by
//! default. When enabled, it is initialized in [`crate::vm::Vm::new`] and
//! shows logs of level INFO or lower by default (configurable via
//! `RUST_LOG`).
//!
//! A host embedding this crate in a larger program may wish to use its own
//! logging setup. In that case, disable the "builtin_env_logger" feature and
//! install a `log` backend of your choosing before constructing a `Vm`.

/// Attempt to init an env_logger for the runtime. Does nothing (beyond a
/// debug-level log line) if the "builtin_env_logger" feature is disabled.
pub(crate) fn try_init() {
    cfg_if::cfg_if! {
        if #[cfg(feature = "builtin_env_logger")] {
            let result = env_logger::try_init_from_env(
                env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
            );
            match result {
                Ok(()) => log::debug!("quickfit-vm initialized the logger."),
                Err(e) => log::debug!("quickfit-vm failed to initialize the built-in env_logger: {e}"),
            }
        } else {
            log::debug!("quickfit-vm did not initialize a logger: the \"builtin_env_logger\" feature is disabled.");
        }
    }
}
