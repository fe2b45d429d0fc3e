#![no_main]
use libfuzzer_sys::fuzz_target;
use notetex_syntax::{DelimiterSpec, concat, scan};

fuzz_target!(|data: &[u8]| {
    let s = String::from_utf8_lossy(data);
    let segments = scan(&s, &DelimiterSpec::defaults());
    assert_eq!(concat(&segments), s);
});
