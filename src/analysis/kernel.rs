//! Kernel classification.
//!
//! Device kernels are recognized through the `nvvm.annotations` metadata
//! list; host-side launch stubs through their (demangled) name.

use crate::ir::{Function, MetadataOperand, Module, KERNEL_ANNOTATIONS};

/// Marker the host compiler puts in front of a kernel's name to name its
/// launch stub.
pub const DEVICE_STUB_MARKER: &str = "__device_stub__";

/// Decides which functions are fission candidates.
pub trait KernelOracle {
    /// Whether `func` is an accelerator entry point.
    fn is_kernel(&self, module: &Module, func: &Function) -> bool;

    /// Whether `func` is a host-side launch stub.
    fn is_launch_stub(&self, func: &Function) -> bool;
}

/// Classification by kernel annotations and stub naming.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnnotationOracle;

impl KernelOracle for AnnotationOracle {
    fn is_kernel(&self, module: &Module, func: &Function) -> bool {
        module.named_nodes(KERNEL_ANNOTATIONS).any(|node| match node {
            [MetadataOperand::Function(name), MetadataOperand::String(kind), MetadataOperand::Int(_, 1)] => {
                name == &func.name && kind == "kernel"
            }
            _ => false,
        })
    }

    fn is_launch_stub(&self, func: &Function) -> bool {
        function_name(&func.name).contains(DEVICE_STUB_MARKER)
    }
}

/// Demangle an Itanium `_Z` symbol down to its qualified name, dropping the
/// parameter encoding. Returns `None` for names that are not mangled or that
/// do not follow the `<len><name>` scheme.
///
/// ```text
/// _Z6vecAddPfS_S_i        -> vecAdd
/// _ZN2ns6kernelEPf        -> ns::kernel
/// ```
pub fn demangle(symbol: &str) -> Option<String> {
    let rest = symbol.strip_prefix("_Z")?;
    let (nested, mut rest) = match rest.strip_prefix('N') {
        Some(inner) => (true, inner),
        None => (false, rest),
    };

    let mut parts = Vec::new();
    loop {
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            break;
        }
        let len: usize = rest[..digits].parse().ok()?;
        let end = digits.checked_add(len)?;
        let name = rest.get(digits..end)?;
        parts.push(name);
        rest = &rest[end..];
        if !nested {
            break;
        }
    }

    if parts.is_empty() || (nested && !rest.starts_with('E')) {
        return None;
    }
    Some(parts.join("::"))
}

/// Name of a function without mangling or parameter list.
pub fn function_name(symbol: &str) -> String {
    demangle(symbol).unwrap_or_else(|| symbol.to_string())
}

/// Device kernel launched by the stub `stub_name`.
///
/// The stub's name past the stub marker must appear in the kernel's
/// demangled name.
pub fn kernel_for_stub<'m>(module: &'m Module, stub_name: &str, oracle: &dyn KernelOracle) -> Option<&'m Function> {
    let name = function_name(stub_name);
    let pos = name.find(DEVICE_STUB_MARKER)?;
    let launched = &name[pos + DEVICE_STUB_MARKER.len()..];
    if launched.is_empty() {
        return None;
    }
    module.functions.iter().find(|f| {
        !oracle.is_launch_stub(f) && oracle.is_kernel(module, f) && function_name(&f.name).contains(launched)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::parse_module;
    use crate::ir::Type;

    const MODULE: &str = r#"
define void @_Z6vecAddPfS_S_i(ptr %A, ptr %B, ptr %C, i32 %N) {
entry:
  ret void
}

define void @_Z21__device_stub__vecAddPfS_S_i(ptr %A, ptr %B, ptr %C, i32 %N) {
entry:
  ret void
}

define void @helper() {
entry:
  ret void
}

!nvvm.annotations = !{!0, !1}
!0 = !{ptr @_Z6vecAddPfS_S_i, !"kernel", i32 1}
!1 = !{ptr @helper, !"maxntidx", i32 256}
"#;

    #[test]
    fn test_demangle() {
        assert_eq!(demangle("_Z6vecAddPfS_S_i").as_deref(), Some("vecAdd"));
        assert_eq!(demangle("_ZN2ns6kernelEPf").as_deref(), Some("ns::kernel"));
        assert_eq!(demangle("_Z21__device_stub__vecAddPfS_S_i").as_deref(), Some("__device_stub__vecAdd"));
        assert_eq!(demangle("main"), None);
        assert_eq!(demangle("_Z99short"), None);
        assert_eq!(function_name("main"), "main");
    }

    #[test]
    fn test_demangle_oversized_length() {
        assert_eq!(demangle("_Z18446744073709551615x"), None);
        assert_eq!(demangle("_ZN18446744073709551615xE"), None);
        assert_eq!(demangle("_Z99999999999999999999999x"), None);
        let func = Function::new("_Z18446744073709551615x", Type::Void, Vec::new());
        assert!(!AnnotationOracle.is_launch_stub(&func));
    }

    #[test]
    fn test_annotation_oracle() {
        let module = parse_module(MODULE).expect("parses");
        let oracle = AnnotationOracle;
        let kernel = &module.functions[0];
        let stub = &module.functions[1];
        let helper = &module.functions[2];

        assert!(oracle.is_kernel(&module, kernel));
        assert!(!oracle.is_kernel(&module, stub));
        assert!(!oracle.is_kernel(&module, helper), "non-kernel annotation is ignored");
        assert!(oracle.is_launch_stub(stub));
        assert!(!oracle.is_launch_stub(kernel));
    }

    #[test]
    fn test_kernel_for_stub() {
        let module = parse_module(MODULE).expect("parses");
        let found = kernel_for_stub(&module, "_Z21__device_stub__vecAddPfS_S_i", &AnnotationOracle)
            .expect("stub pairs with its kernel");
        assert_eq!(found.name, "_Z6vecAddPfS_S_i");
        assert!(kernel_for_stub(&module, "helper", &AnnotationOracle).is_none());
        assert!(kernel_for_stub(&module, "__device_stub__missing", &AnnotationOracle).is_none());
    }
}
