use gfx_hal::pso;
use std::fmt;
use std::io::{Cursor, Read};

use crate::error::ShaderError;

pub const VERTEX_SHADER: &str = include_str!("../data/triangle.vert");
pub const FIRST_FRAGMENT_SHADER: &str = include_str!("../data/first.frag");
pub const SECOND_FRAGMENT_SHADER: &str = include_str!("../data/second.frag");

/// Upper bound on the compiler log kept in a `ShaderError`.
pub const INFO_LOG_CAPACITY: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => f.write_str("vertex"),
            ShaderStage::Fragment => f.write_str("fragment"),
        }
    }
}

impl ShaderStage {
    fn shader_type(self) -> glsl_to_spirv::ShaderType {
        match self {
            ShaderStage::Vertex => glsl_to_spirv::ShaderType::Vertex,
            ShaderStage::Fragment => glsl_to_spirv::ShaderType::Fragment,
        }
    }
}

/// Compiles GLSL source into SPIR-V words.
pub fn compile(stage: ShaderStage, source: &str) -> Result<Vec<u32>, ShaderError> {
    let mut file = glsl_to_spirv::compile(source, stage.shader_type()).map_err(|log| {
        ShaderError::Compilation {
            stage,
            log: truncate_log(log),
        }
    })?;

    let mut buf = vec![];
    file.read_to_end(&mut buf).map_err(|source| ShaderError::InvalidSpirv { stage, source })?;

    let spirv = pso::read_spirv(Cursor::new(&buf[..]))
        .map_err(|source| ShaderError::InvalidSpirv { stage, source })?;
    log::debug!("compiled {} shader into {} words", stage, spirv.len());
    Ok(spirv)
}

fn truncate_log(mut log: String) -> String {
    if log.len() > INFO_LOG_CAPACITY {
        let mut end = INFO_LOG_CAPACITY;
        while !log.is_char_boundary(end) {
            end -= 1;
        }
        log.truncate(end);
    }
    log
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[test]
    fn embedded_shaders_compile() {
        for (stage, source) in vec![
            (ShaderStage::Vertex, VERTEX_SHADER),
            (ShaderStage::Fragment, FIRST_FRAGMENT_SHADER),
            (ShaderStage::Fragment, SECOND_FRAGMENT_SHADER),
        ] {
            let spirv = compile(stage, source).unwrap();
            assert_eq!(spirv[0], SPIRV_MAGIC);
        }
    }

    #[test]
    fn broken_shader_reports_stage() {
        let source = "#version 450\nvoid main() { this is not glsl }\n";
        match compile(ShaderStage::Fragment, source) {
            Err(ShaderError::Compilation { stage, log }) => {
                assert_eq!(stage, ShaderStage::Fragment);
                assert!(log.len() <= INFO_LOG_CAPACITY);
            }
            other => panic!("expected a compilation error, got {:?}", other),
        }
    }

    #[test]
    fn long_log_is_cut_to_capacity() {
        let log = "x".repeat(INFO_LOG_CAPACITY + 100);
        assert_eq!(truncate_log(log).len(), INFO_LOG_CAPACITY);
    }

    #[test]
    fn truncation_keeps_utf8_intact() {
        // 'é' is two bytes, so byte 512 falls inside a char.
        let log = format!("x{}", "é".repeat(INFO_LOG_CAPACITY));
        let cut = truncate_log(log);
        assert_eq!(cut.len(), INFO_LOG_CAPACITY - 1);
        assert!(cut.ends_with('é'));
    }

    #[test]
    fn short_log_is_untouched() {
        assert_eq!(truncate_log("oops".to_owned()), "oops");
    }
}
