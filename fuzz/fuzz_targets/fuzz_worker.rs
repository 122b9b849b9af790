#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Garbage requests must come back as protocol errors. Only well-formed
    // requests reach synthesis, and those name no real backend here.
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(mut request) = serde_json::from_str::<palisade_engine::WorkerRequest>(text) {
            request.job.params.solver = "fuzz".into();
            request.job.degree = request.job.degree.min(4);
            let Ok(mut payload) = serde_json::to_vec(&request) else {
                return;
            };
            payload.push(b'\n');
            let mut out = Vec::new();
            let _ = palisade_engine::serve_worker(std::io::Cursor::new(payload), &mut out);
        }
    }
});
