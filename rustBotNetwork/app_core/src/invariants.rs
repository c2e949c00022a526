use crate::contracts::PipelineError;

/// # NDOC
/// component: `app_core::invariants`
/// purpose: Shared invariant checks used by multiple subsystems.
/// invariants:
///   - Validation helpers must return `PipelineError::validation` for caller-safe failures.
///   - Helpers must not perform I/O or mutate external state.
pub fn ensure_non_empty_trimmed(value: &str, field: &str) -> Result<(), PipelineError> {
    if value.trim().is_empty() {
        return Err(PipelineError::validation(format!(
            "'{}' cannot be empty",
            field
        )));
    }
    Ok(())
}

/// # NDOC
/// component: `app_core::invariants`
/// purpose: Enforce an inclusive numeric bound with a user-safe error.
/// invariants:
///   - `name` is used directly in error messages and should be stable.
pub fn ensure_range_usize(
    value: usize,
    min: usize,
    max: usize,
    name: &str,
) -> Result<(), PipelineError> {
    if value < min || value > max {
        return Err(PipelineError::validation(format!(
            "'{}' must be in range {}..={}",
            name, min, max
        )));
    }
    Ok(())
}

/// # NDOC
/// component: `app_core::invariants`
/// purpose: Ensure JSON pointer strings are explicit and deterministic.
/// invariants:
///   - JSON pointer paths must start with `/` to avoid ambiguous parsing.
pub fn ensure_json_pointer(path: &str, field: &str) -> Result<(), PipelineError> {
    if !path.starts_with('/') {
        return Err(PipelineError::validation(format!(
            "'{}' must be a JSON pointer starting with '/'",
            field
        )));
    }
    Ok(())
}

/// Enforce a closed-interval float bound, used pervasively for confidence,
/// impact, and score fields that the data model pins to `[0,1]` or `[0,10]`.
pub fn ensure_unit_range(value: f64, name: &str) -> Result<(), PipelineError> {
    ensure_range_f64(value, 0.0, 1.0, name)
}

pub fn ensure_range_f64(value: f64, min: f64, max: f64, name: &str) -> Result<(), PipelineError> {
    if !value.is_finite() || value < min || value > max {
        return Err(PipelineError::validation(format!(
            "'{}' must be a finite value in range {}..={}, got {}",
            name, min, max, value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Naming scheme: inv_global_<domain>_<nnn>_<behavior>
    #[test]
    fn inv_global_core_001_rejects_empty_trimmed_string() {
        let err = ensure_non_empty_trimmed("   ", "topic").expect_err("must fail");
        assert!(err.to_string().contains("topic"));
    }

    #[test]
    fn inv_global_core_002_validates_usize_range() {
        assert!(ensure_range_usize(5, 1, 10, "max_sources").is_ok());
        assert!(ensure_range_usize(11, 1, 10, "max_sources").is_err());
    }

    #[test]
    fn inv_global_core_003_validates_json_pointer_prefix() {
        assert!(ensure_json_pointer("/foo/bar", "path").is_ok());
        assert!(ensure_json_pointer("foo/bar", "path").is_err());
    }

    #[test]
    fn inv_global_core_004_unit_range_rejects_out_of_bounds() {
        assert!(ensure_unit_range(0.5, "confidence").is_ok());
        assert!(ensure_unit_range(1.1, "confidence").is_err());
        assert!(ensure_unit_range(f64::NAN, "confidence").is_err());
    }
}
