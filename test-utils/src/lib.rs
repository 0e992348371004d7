//! `test-utils` is used for testing in both `fetchgate-lib` and `fetchgate-bin`.
//! This crate does not depend on `fetchgate-lib` or `fetchgate-bin`, else we would get dependency cycles.
//! Macros are used instead, so that the importer is responsible for providing the dependencies.

/// Create a mock web server, which responds with a predefined status when
/// handling a matching request
#[macro_export]
macro_rules! mock_server {
    ($status:expr $(, $func:tt ($($arg:expr),*))*) => {{
        let mock_server = wiremock::MockServer::start().await;
        let response_template = wiremock::ResponseTemplate::new(http::StatusCode::from($status));
        let template = response_template$(.$func($($arg),*))*;
        wiremock::Mock::given(wiremock::matchers::method("GET")).respond_with(template).mount(&mock_server).await;
        mock_server
    }};
}

/// Create a mock web server, which answers the first `$throttled` requests
/// with `429 Too Many Requests` and every later one with the given template
#[macro_export]
macro_rules! throttling_mock_server {
    ($throttled:expr, $status:expr $(, $func:tt ($($arg:expr),*))*) => {{
        let mock_server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(http::StatusCode::TOO_MANY_REQUESTS))
            .up_to_n_times($throttled)
            .mount(&mock_server)
            .await;
        let response_template = wiremock::ResponseTemplate::new(http::StatusCode::from($status));
        let template = response_template$(.$func($($arg),*))*;
        wiremock::Mock::given(wiremock::matchers::method("GET")).respond_with(template).mount(&mock_server).await;
        mock_server
    }};
}

/// Parse a URL relative to the root of a mock server
///
/// # Panic
///
/// This panics if the result is not a valid URL, so it should only be used for
/// testing
#[macro_export]
macro_rules! mock_url {
    ($server:expr, $path:expr) => {
        url::Url::parse(&format!("{}{}", $server.uri(), $path)).expect("Expected valid mock URL")
    };
}
