use upload_tracker::config::Config;
use upload_tracker::utils::{sanitize_filename, token_fingerprint};

#[test]
fn test_sanitize_filename() {
    // basic alphanumeric with extension
    assert_eq!(sanitize_filename("clip.mp4"), "clip.mp4");

    // only the last path segment is sent
    assert_eq!(sanitize_filename("../clip.mp4"), "clip.mp4");
    assert_eq!(sanitize_filename("videos/2024/clip.mp4"), "clip.mp4");
    assert_eq!(sanitize_filename("C:\\Users\\me\\clip.mp4"), "clip.mp4");

    // special characters
    assert_eq!(sanitize_filename("my-clip_01.mp4"), "my-clip_01.mp4");
    assert_eq!(sanitize_filename("clip one (final).mp4"), "cliponefinal.mp4");

    // leading dots
    assert_eq!(sanitize_filename(".hidden.mov"), "hidden.mov");
    assert_eq!(sanitize_filename("..."), "");
}

#[test]
fn test_token_fingerprint() {
    assert_eq!(token_fingerprint(""), "<unset>");

    let fingerprint = token_fingerprint("secret-token");
    assert_eq!(fingerprint.len(), 12);
    assert!(Config::hash_api_key("secret-token").starts_with(&fingerprint));
    assert!(!fingerprint.contains("secret"));
}
