use crate::error::KVError;

/// Check that a silo name can double as a directory name and an entity kind.
pub fn validate(namespace: &str) -> Result<(), KVError> {
    if namespace.is_empty() {
        return Err(KVError::OpenFailed("silo name is empty".to_string()));
    }
    if namespace == "." || namespace == ".." {
        return Err(KVError::OpenFailed(format!("invalid silo name: {:?}", namespace)));
    }
    if namespace.contains(['/', '\\', '\0']) {
        return Err(KVError::OpenFailed(format!(
            "silo name must not contain path separators: {:?}",
            namespace
        )));
    }
    Ok(())
}
