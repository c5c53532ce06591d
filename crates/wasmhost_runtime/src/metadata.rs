use wasmparser::{Encoding, Parser, Payload};

use crate::error::LoadError;

#[derive(Debug, Clone, Default)]
pub struct ModuleMetadata {
    /// Function index of the start routine, if any.
    pub start: Option<u32>,
    /// Names of custom sections in file order (e.g. `name`, `producers`).
    pub custom_sections: Vec<String>,
}

impl ModuleMetadata {
    pub fn has_start(&self) -> bool {
        self.start.is_some()
    }
}

/// Precondition: data is a binary of the WASM module.
pub(crate) fn scan(data: &[u8]) -> Result<ModuleMetadata, LoadError> {
    let mut metadata = ModuleMetadata::default();
    for payload in Parser::new(0).parse_all(data) {
        let payload = payload.map_err(|e| LoadError::InvalidBinary(e.to_string()))?;
        match payload {
            Payload::Version { encoding, .. } => {
                if encoding == Encoding::Component {
                    return Err(LoadError::InvalidBinary(
                        "components are not supported, expected a core module".to_string(),
                    ));
                }
            }
            Payload::StartSection { func, .. } => {
                metadata.start = Some(func);
            }
            Payload::CustomSection(section) => {
                metadata.custom_sections.push(section.name().to_string());
            }
            Payload::End(_) => {
                break;
            }
            _ => {}
        }
    }
    tracing::debug!(
        "module metadata: start={:?}, {} custom sections",
        metadata.start,
        metadata.custom_sections.len()
    );
    Ok(metadata)
}
