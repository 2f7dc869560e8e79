use super::*;

#[test]
fn display_prefixes_are_stable() {
    assert!(
        LifeframeError::setup("x")
            .to_string()
            .contains("setup error:")
    );
    assert!(
        LifeframeError::precondition("x")
            .to_string()
            .contains("precondition violated:")
    );
    assert!(
        LifeframeError::device("x")
            .to_string()
            .contains("device execution error:")
    );
    assert!(
        LifeframeError::config("x")
            .to_string()
            .contains("configuration error:")
    );
}

#[test]
fn pacing_timeout_names_the_frame() {
    let err = LifeframeError::PacingTimeout {
        frame: 7,
        waited_ms: 250,
    };
    let msg = err.to_string();
    assert!(msg.contains("frame 7"));
    assert!(msg.contains("250 ms"));
    assert!(err.is_device_loss());
}

#[test]
fn setup_errors_are_not_device_loss() {
    assert!(!LifeframeError::setup("missing entry point").is_device_loss());
    assert!(LifeframeError::device("lost").is_device_loss());
}

#[test]
fn other_preserves_source() {
    let base = std::io::Error::other("boom");
    let err = LifeframeError::Other(anyhow::Error::new(base));
    assert!(err.to_string().contains("boom"));
}
