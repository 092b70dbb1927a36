#![no_main]
use blockspace::DiskBitmap;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Malformed images must be rejected, never panic
    if let Ok(bitmap) = DiskBitmap::from_bytes(data) {
        assert_eq!(bitmap.to_bytes(), data);
    }
});
