// SPDX-License-Identifier: GPL-3.0-only

//! Named GPU program registry
//!
//! Execution contexts resolve programs by function name. The library maps
//! each name to the WGSL source that defines it, the entry point and the
//! pipeline stage, so a context can compile it on first use.

use crate::errors::GpuError;
use std::collections::HashMap;
use std::sync::Arc;

/// Full-screen quad vertex stage
pub const BASIC_VERTEX: &str = "basic_vertex";
/// Samples the input texture at the interpolated coordinate
pub const BASIC_FRAGMENT: &str = "basic_fragment";
pub const GRAYSCALE_COMPUTE: &str = "grayscale_compute";
pub const SEPIA_COMPUTE: &str = "sepia_compute";
pub const PASSTHROUGH_COMPUTE: &str = "passthrough_compute";

const BASIC_WGSL: &str = include_str!("programs/basic.wgsl");
const GRAYSCALE_WGSL: &str = include_str!("programs/grayscale.wgsl");
const SEPIA_WGSL: &str = include_str!("programs/sepia.wgsl");
const PASSTHROUGH_WGSL: &str = include_str!("programs/passthrough.wgsl");

/// Pipeline stage a function runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

/// One entry point inside a WGSL module
#[derive(Debug, Clone)]
pub struct ShaderFunction {
    pub name: String,
    pub stage: ShaderStage,
    pub source: Arc<str>,
}

impl ShaderFunction {
    /// Entry point name inside the module (functions are registered under their WGSL name)
    pub fn entry_point(&self) -> &str {
        &self.name
    }
}

/// Registry of every function a context can resolve
#[derive(Debug, Clone, Default)]
pub struct ProgramLibrary {
    functions: HashMap<String, ShaderFunction>,
}

impl ProgramLibrary {
    /// Empty library (tests and custom setups)
    pub fn new() -> Self {
        Self::default()
    }

    /// Library with the bundled quad, grayscale, sepia and passthrough programs
    pub fn with_builtins() -> Self {
        let mut library = Self::new();
        library.register_module(
            BASIC_WGSL,
            &[
                (BASIC_VERTEX, ShaderStage::Vertex),
                (BASIC_FRAGMENT, ShaderStage::Fragment),
            ],
        );
        library.register_module(GRAYSCALE_WGSL, &[(GRAYSCALE_COMPUTE, ShaderStage::Compute)]);
        library.register_module(SEPIA_WGSL, &[(SEPIA_COMPUTE, ShaderStage::Compute)]);
        library.register_module(
            PASSTHROUGH_WGSL,
            &[(PASSTHROUGH_COMPUTE, ShaderStage::Compute)],
        );
        library
    }

    /// Register every listed entry point of one WGSL module
    ///
    /// Re-registering a name replaces the previous definition.
    pub fn register_module(&mut self, source: &str, functions: &[(&str, ShaderStage)]) {
        let source: Arc<str> = Arc::from(source);
        for (name, stage) in functions {
            self.functions.insert(
                (*name).to_string(),
                ShaderFunction {
                    name: (*name).to_string(),
                    stage: *stage,
                    source: Arc::clone(&source),
                },
            );
        }
    }

    /// Look up a function, checking it runs in the expected stage
    pub fn function(&self, name: &str, stage: ShaderStage) -> Result<&ShaderFunction, GpuError> {
        match self.functions.get(name) {
            Some(function) if function.stage == stage => Ok(function),
            Some(function) => Err(GpuError::PipelineCreation(format!(
                "{} is a {:?} function, expected {:?}",
                name, function.stage, stage
            ))),
            None => Err(GpuError::ProgramNotFound(name.to_string())),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Sorted function names with their stage
    pub fn entries(&self) -> Vec<(&str, ShaderStage)> {
        let mut entries: Vec<_> = self
            .functions
            .values()
            .map(|f| (f.name.as_str(), f.stage))
            .collect();
        entries.sort_by_key(|(name, _)| *name);
        entries
    }

    /// Distinct WGSL sources, for validation
    pub fn sources(&self) -> Vec<Arc<str>> {
        let mut sources: Vec<Arc<str>> = Vec::new();
        for function in self.functions.values() {
            if !sources.iter().any(|s| Arc::ptr_eq(s, &function.source)) {
                sources.push(Arc::clone(&function.source));
            }
        }
        sources
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Validate that a WGSL module parses and validates using naga
    fn validate_shader(source: &str) {
        match naga::front::wgsl::parse_str(source) {
            Ok(module) => {
                let info = naga::valid::Validator::new(
                    naga::valid::ValidationFlags::all(),
                    naga::valid::Capabilities::all(),
                )
                .validate(&module);

                if let Err(e) = info {
                    panic!("Shader validation failed: {:?}\n{}", e, source);
                }
            }
            Err(e) => {
                panic!("Shader parse failed: {:?}\n{}", e, source);
            }
        }
    }

    #[test]
    fn test_builtin_shaders_validate() {
        let library = ProgramLibrary::with_builtins();
        let sources = library.sources();
        assert_eq!(sources.len(), 4);
        for source in sources {
            validate_shader(&source);
        }
    }

    #[test]
    fn test_lookup_checks_stage() {
        let library = ProgramLibrary::with_builtins();
        assert!(library.function(BASIC_VERTEX, ShaderStage::Vertex).is_ok());
        assert!(matches!(
            library.function(BASIC_VERTEX, ShaderStage::Compute),
            Err(GpuError::PipelineCreation(_))
        ));
        assert_eq!(
            library
                .function("missing", ShaderStage::Compute)
                .unwrap_err(),
            GpuError::ProgramNotFound("missing".into())
        );
    }

    #[test]
    fn test_entries_sorted() {
        let library = ProgramLibrary::with_builtins();
        let names: Vec<&str> = library.entries().into_iter().map(|(n, _)| n).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert_eq!(names.len(), 5);
    }
}
