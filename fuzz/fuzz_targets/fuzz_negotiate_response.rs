#![no_main]

use libfuzzer_sys::fuzz_target;
use signalr_connect::negotiate::validate_response;
use signalr_connect::HttpResponse;

fuzz_target!(|data: &[u8]| {
    // Negotiate bodies are arbitrary server output; validation must never panic.
    if let Ok(body) = std::str::from_utf8(data) {
        let _ = validate_response(&HttpResponse::new(200, body));
    }
});
