//! Unit tests for the application error enumeration.

use host_harness::AppError;

#[test]
fn display_prefixes_identify_the_domain() {
    assert_eq!(
        AppError::Connect("no candidates".into()).to_string(),
        "connect: no candidates"
    );
    assert_eq!(
        AppError::Protocol("bad line".into()).to_string(),
        "protocol: bad line"
    );
    assert_eq!(
        AppError::Marshal("queue gone".into()).to_string(),
        "marshal: queue gone"
    );
    assert_eq!(
        AppError::Resource("cannot open".into()).to_string(),
        "resource: cannot open"
    );
    assert_eq!(AppError::Cancelled.to_string(), "cancelled");
}

#[test]
fn io_errors_convert() {
    let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe gone");
    let err: AppError = io.into();
    assert!(matches!(err, AppError::Io(_)));
    assert!(err.to_string().contains("pipe gone"));
}
