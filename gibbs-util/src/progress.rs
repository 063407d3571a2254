use indicatif::{ProgressBar, ProgressStyle};

/// Progress bar of length `len` drawn with an indicatif `template`, e.g.
/// `"Gibbs {bar:40} {pos}/{len} sweeps ({eta})"`. Falls back to the
/// default style if the template does not parse.
pub fn new_progress_bar(len: u64, template: &str) -> ProgressBar {
    let style = ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    ProgressBar::new(len).with_style(style)
}
