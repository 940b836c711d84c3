/// Set to skip launching a browser; the URL is still printed.
pub const NO_BROWSER_ENV: &str = "TASKLINK_NO_BROWSER";

/// Print `url` on stderr and try to open it in the default browser.
/// Stdout is left alone so hook output stays a single JSON document.
pub fn open_url(url: &str) {
    eprintln!("Open this URL to continue:\n  {url}");
    if std::env::var_os(NO_BROWSER_ENV).is_some() {
        return;
    }
    if let Err(e) = open::that(url) {
        tracing::warn!("could not open browser: {e}");
    }
}
