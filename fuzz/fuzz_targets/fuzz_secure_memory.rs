#![no_main]

use arbitrary::Arbitrary;
use keyseal::secure_memory::SecureBytes;
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct SecureMemoryFuzzInput {
    data: Vec<u8>,
    clear: bool,
}

fuzz_target!(|input: SecureMemoryFuzzInput| {
    let mut secure = SecureBytes::new(&input.data);
    assert_eq!(secure.as_bytes(), &input.data[..]);
    assert_eq!(secure.len(), input.data.len());

    // Debug output never contains the contents
    let printed = format!("{:?}", secure);
    assert!(printed.contains("REDACTED"));

    let cloned = secure.clone();
    if input.clear {
        secure.clear();
        assert!(secure.is_empty());
        assert_eq!(cloned.as_bytes(), &input.data[..]);
    } else {
        assert_eq!(secure.into_vec(), input.data);
    }
});
