use std::{env, path::Path};

/**
 * Help tests find their fixture files.
 *
 * If we invoke tests via 'cargo test', the base dir is the crate dir (e.g.,
 * firehose/libfirehose) but if we start it from an IDE it's usually the
 * workspace root, so try both.
 */

pub fn test_dir(base: &str, f: &str) -> String {
    use std::fs::metadata;
    if metadata(f).is_ok() {
        return f.to_string();
    }
    let p = Path::new(base).join(f);
    if metadata(&p).is_ok() {
        p.to_string_lossy().into_owned()
    } else {
        let cwd = env::current_dir()
            .map(|d| d.display().to_string())
            .unwrap_or_else(|_| "<unknown>".to_string());
        panic!("Couldn't find test fixture {} (base {}) from cwd={}", f, base, cwd);
    }
}
