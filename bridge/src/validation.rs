//! WASM module validation — guest ABI checks.
//!
//! Validates that a compiled WASM module meets the Tessel guest ABI before
//! it can be instantiated. Checks:
//!
//! 1. Required exports present with correct signatures
//! 2. Optional `__tessel_realloc` correctly typed if present
//! 3. A funcref table export for closure invokers and destructors
//! 4. All imports are functions from the `tessel` module, no WASI

use wasmtime::{ExternType, FuncType, Module, RefType, ValType};

use crate::error::BridgeError;
use crate::surface::IMPORT_MODULE;

pub const MEMORY_EXPORT: &str = "memory";
pub const MALLOC_EXPORT: &str = "__tessel_malloc";
pub const REALLOC_EXPORT: &str = "__tessel_realloc";
pub const START_EXPORT: &str = "__tessel_start";
pub const TABLE_EXPORT: &str = "__tessel_table";

/// Check if a ValType is i32.
fn is_i32(vt: &ValType) -> bool {
    matches!(vt, ValType::I32)
}

/// Expected export: (name, param_count_of_i32, result_count_of_i32).
const REQUIRED_EXPORTS: &[(&str, usize, usize)] = &[(MALLOC_EXPORT, 1, 1), (START_EXPORT, 0, 0)];

/// Optional exports, checked only when present.
const OPTIONAL_EXPORTS: &[(&str, usize, usize)] = &[(REALLOC_EXPORT, 3, 1)];

/// Validate that a WASM module meets the guest ABI.
pub fn validate_module(module: &Module) -> Result<(), BridgeError> {
    validate_exports(module)?;
    validate_imports(module)?;
    Ok(())
}

/// Check that all required exports are present with correct signatures.
fn validate_exports(module: &Module) -> Result<(), BridgeError> {
    let has_memory = module
        .exports()
        .any(|e| e.name() == MEMORY_EXPORT && matches!(e.ty(), ExternType::Memory(_)));
    if !has_memory {
        return Err(BridgeError::ValidationError(format!(
            "module must export '{}'",
            MEMORY_EXPORT
        )));
    }

    let has_table = module.exports().any(|e| {
        e.name() == TABLE_EXPORT
            && matches!(e.ty(), ExternType::Table(t) if t.element().matches(&RefType::FUNCREF))
    });
    if !has_table {
        return Err(BridgeError::ValidationError(format!(
            "module must export funcref table '{}'",
            TABLE_EXPORT
        )));
    }

    for &(name, params, results) in REQUIRED_EXPORTS {
        let export = module
            .exports()
            .find(|e| e.name() == name)
            .ok_or_else(|| BridgeError::ValidationError(format!("missing required export: {}", name)))?;
        check_signature(name, export.ty(), params, results)?;
    }

    for &(name, params, results) in OPTIONAL_EXPORTS {
        if let Some(export) = module.exports().find(|e| e.name() == name) {
            check_signature(name, export.ty(), params, results)?;
        }
    }

    Ok(())
}

fn check_signature(
    name: &str,
    ty: ExternType,
    expected_param_count: usize,
    expected_result_count: usize,
) -> Result<(), BridgeError> {
    let func_ty: FuncType = match ty {
        ExternType::Func(ft) => ft,
        _ => {
            return Err(BridgeError::ValidationError(format!(
                "export '{}' must be a function",
                name
            )));
        }
    };

    let params: Vec<ValType> = func_ty.params().collect();
    let results: Vec<ValType> = func_ty.results().collect();

    if params.len() != expected_param_count || !params.iter().all(is_i32) {
        return Err(BridgeError::ValidationError(format!(
            "export '{}' has wrong param signature: expected {} i32 params, got {} params",
            name,
            expected_param_count,
            params.len()
        )));
    }

    if results.len() != expected_result_count || !results.iter().all(is_i32) {
        return Err(BridgeError::ValidationError(format!(
            "export '{}' has wrong result signature: expected {} i32 results, got {} results",
            name,
            expected_result_count,
            results.len()
        )));
    }

    Ok(())
}

/// Check that all imports are from `tessel` and none are WASI.
fn validate_imports(module: &Module) -> Result<(), BridgeError> {
    for import in module.imports() {
        let module_name = import.module();

        // Reject WASI imports
        if module_name.starts_with("wasi") {
            return Err(BridgeError::ValidationError(format!(
                "WASI import not allowed: {}::{}",
                module_name,
                import.name()
            )));
        }

        if module_name != IMPORT_MODULE {
            return Err(BridgeError::ValidationError(format!(
                "import from unknown module '{}' (only '{}' allowed): {}",
                module_name,
                IMPORT_MODULE,
                import.name()
            )));
        }

        // Imports must be functions
        if !matches!(import.ty(), ExternType::Func(_)) {
            return Err(BridgeError::ValidationError(format!(
                "non-function import not allowed: {}::{}",
                module_name,
                import.name()
            )));
        }
    }

    Ok(())
}
