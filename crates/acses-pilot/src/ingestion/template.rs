use std::path::Path;

use super::IngestError;
use crate::pipeline::PromptTemplate;

/// Read and validate the master prompt template.
pub fn load_template(path: &Path) -> Result<PromptTemplate, IngestError> {
    let body = std::fs::read_to_string(path).map_err(|source| IngestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    PromptTemplate::new(body).map_err(|source| IngestError::Template {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::TemplateError;
    use tempfile::TempDir;

    #[test]
    fn rejects_template_without_placeholders() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("master_prompt.txt");
        std::fs::write(&path, "Periksa {job_description} saja.").unwrap();

        match load_template(&path) {
            Err(IngestError::Template {
                source: TemplateError::MissingPlaceholders { missing },
                ..
            }) => assert_eq!(missing.len(), 2),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn loads_valid_template() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("master_prompt.txt");
        std::fs::write(
            &path,
            "{job_description}\n{code_to_check}\n{hierarchy_context}\n",
        )
        .unwrap();
        assert!(load_template(&path).is_ok());
        assert!(matches!(
            load_template(&temp.path().join("missing.txt")),
            Err(IngestError::Io { .. })
        ));
    }
}
