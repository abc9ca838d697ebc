//! Session event subscribers. A plugin declares which events it cares about
//! simply by overriding the corresponding method; every other event is a
//! no-op. Plugins may only act through the arguments handed to them — they
//! never reach into session-private state.

pub mod builtin;

use cairn_hash::Hash;

use crate::{error::Error, rule::RuleId};

pub type PluginResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// An event subscriber installed on a [`crate::Session`] for its lifetime.
/// Handlers run synchronously, in registration order; one returning an
/// error aborts the session with [`Error::PluginError`](crate::Error::PluginError).
pub trait Plugin {
    fn session_open(&mut self) -> PluginResult {
        Ok(())
    }

    fn session_close(&mut self) -> PluginResult {
        Ok(())
    }

    fn task_created(&mut self, fingerprint: Hash, rule: RuleId) -> PluginResult {
        let _ = (fingerprint, rule);
        Ok(())
    }

    fn task_ready(&mut self, fingerprint: Hash) -> PluginResult {
        let _ = fingerprint;
        Ok(())
    }

    fn task_run_start(&mut self, fingerprint: Hash) -> PluginResult {
        let _ = fingerprint;
        Ok(())
    }

    fn task_run_end(&mut self, fingerprint: Hash) -> PluginResult {
        let _ = fingerprint;
        Ok(())
    }

    fn task_done(&mut self, fingerprint: Hash) -> PluginResult {
        let _ = fingerprint;
        Ok(())
    }

    fn task_error(&mut self, fingerprint: Hash, error: &Error) -> PluginResult {
        let _ = (fingerprint, error);
        Ok(())
    }

    fn post_enter(&mut self) -> PluginResult {
        Ok(())
    }

    fn pre_exit(&mut self) -> PluginResult {
        Ok(())
    }
}
