#![no_main]
use cfb_store::{CompoundFile, CompoundFileBuilder};
use libfuzzer_sys::fuzz_target;

// Arbitrary bytes must open cleanly or fail with an error, never panic or hang
fuzz_target!(|data: &[u8]| {
    let mut file = match CompoundFile::open_bytes(data.to_vec()) {
        Ok(file) => file,
        Err(_) => return,
    };

    if let Ok(entries) = file.walk() {
        for entry in entries.iter().filter(|e| e.is_stream()) {
            let _ = file.read_stream(&entry.path);
        }
    }

    // Whatever opened must write out to something that opens again
    if let Ok(bytes) = file.to_bytes() {
        let _ = CompoundFileBuilder::new()
            .validate_on_open(false)
            .open_bytes(bytes);
    }
});
