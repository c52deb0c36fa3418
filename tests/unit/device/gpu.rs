use super::*;

#[test]
fn every_builtin_has_a_shader() {
    for sig in builtin::ALL {
        assert!(kernel_source(&sig).is_some(), "{}", sig.name);
    }
}

#[test]
fn shaders_declare_their_signature() {
    for sig in builtin::ALL {
        let src = kernel_source(&sig).unwrap();
        let storage = format!("var<storage, read_write> {}:", sig.buffer_binding);
        assert!(src.contains(&storage), "{}: {storage}", sig.name);
        for field in [sig.uniforms.width, sig.uniforms.height, sig.uniforms.sample] {
            assert!(src.contains(&format!("    {field}: ")), "{}: {field}", sig.name);
        }
        let wg = format!("@workgroup_size({0}, {0}, 1)", sig.local_size);
        assert!(src.contains(&wg), "{}", sig.name);
    }
}

#[test]
fn uniform_block_fits_the_binding() {
    assert_eq!(UNIFORM_BLOCK_SIZE, 16);
}
