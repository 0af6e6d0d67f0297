use crate::RuntimeError;

/// Map a managed host's base image name to the account playbooks log in as.
pub fn default_system_user(image_name: &str) -> Result<&'static str, RuntimeError> {
    let lower = image_name.to_ascii_lowercase();
    if lower.contains("debian") {
        Ok("debian")
    } else if lower.contains("ubuntu") {
        Ok("ubuntu")
    } else {
        Err(RuntimeError::UnknownImage(image_name.to_owned()))
    }
}
