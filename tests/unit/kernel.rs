use super::*;
use crate::device::CpuDevice;

#[test]
fn resolves_known_names() {
    let dev = CpuDevice::new();
    let reg = KernelRegistry::default();
    let k = reg.resolve(&dev, "Invert").unwrap();
    assert_eq!(k.name(), "Invert");
    assert_eq!(dev.signatures()[k.index], k.signature);
}

#[test]
fn empty_name_falls_back_to_default() {
    let dev = CpuDevice::new();
    let reg = KernelRegistry::default();
    for blank in ["", "   ", "\t"] {
        let k = reg.resolve(&dev, blank).unwrap();
        assert_eq!(k.name(), DEFAULT_KERNEL);
    }
}

#[test]
fn unknown_name_is_not_replaced() {
    let dev = CpuDevice::new();
    let reg = KernelRegistry::default();
    let err = reg.resolve(&dev, "FilterComputr").unwrap_err();
    assert!(matches!(err, FilterError::KernelNotFound { ref name } if name == "FilterComputr"));
}

#[test]
fn unresolvable_fallback_is_reported_by_its_own_name() {
    let dev = CpuDevice::new();
    let reg = KernelRegistry::new("Sharpen");
    let err = reg.resolve(&dev, "").unwrap_err();
    assert!(matches!(err, FilterError::KernelNotFound { ref name } if name == "Sharpen"));
    // A real name still resolves with a broken fallback.
    assert!(reg.resolve(&dev, "Identity").is_ok());
}

#[test]
fn surrounding_whitespace_is_ignored() {
    let dev = CpuDevice::new();
    let k = KernelRegistry::default().resolve(&dev, " ImageFilter ").unwrap();
    assert_eq!(k.signature, builtin::POSTERIZE);
}

#[test]
fn lists_the_device_kernel_set() {
    let dev = CpuDevice::new();
    assert_eq!(
        KernelRegistry::kernel_names(&dev),
        vec!["Identity", "Invert", "FilterComputer", "ImageFilter"]
    );
}

#[test]
fn builtin_signatures_agree_on_local_size() {
    for sig in builtin::ALL {
        assert_eq!(sig.local_size, crate::dispatch::THREAD_GROUP_SIZE, "{}", sig.name);
    }
}

#[test]
fn handle_display_names_kernel_and_slot() {
    let dev = CpuDevice::new();
    let k = KernelRegistry::default().resolve(&dev, "Invert").unwrap();
    assert_eq!(k.to_string(), "Invert#1");
}
