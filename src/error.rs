use std::fmt;

use crate::renderer::shader::ShaderStage;

#[derive(Debug, thiserror::Error)]
pub enum ShaderError {
    #[error("{stage} shader compilation failed:\n{log}")]
    Compilation { stage: ShaderStage, log: String },

    #[error("{stage} shader produced invalid SPIR-V: {source}")]
    InvalidSpirv {
        stage: ShaderStage,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that stop the renderer from starting or running.
#[derive(Debug, thiserror::Error)]
pub enum RendererError {
    #[error("failed to create window: {0}")]
    Window(String),

    #[error("no adapter exposes a graphics queue that can present to the window")]
    NoGraphicsQueue,

    #[error("no CPU-visible memory type can hold the vertex buffer")]
    NoUploadMemory,

    #[error("`{call}` failed: {reason}")]
    Device { call: &'static str, reason: String },
}

/// Wraps a failed gfx call so the message names the call.
pub fn call_failed<E: fmt::Debug>(call: &'static str) -> impl FnOnce(E) -> RendererError {
    move |err| RendererError::Device {
        call,
        reason: format!("{:?}", err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_error_names_the_call() {
        let err = Err::<(), _>("lost").map_err(call_failed("wait_for_fence")).unwrap_err();
        assert_eq!(err.to_string(), "`wait_for_fence` failed: \"lost\"");
    }

    #[test]
    fn compilation_error_shows_stage_and_log() {
        let err = ShaderError::Compilation {
            stage: ShaderStage::Fragment,
            log: "ERROR: 0:3: syntax error".to_owned(),
        };
        assert_eq!(
            err.to_string(),
            "fragment shader compilation failed:\nERROR: 0:3: syntax error"
        );
    }
}
