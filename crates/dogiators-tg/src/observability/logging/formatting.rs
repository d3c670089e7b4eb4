use std::fmt;
use std::time::Duration;

#[must_use]
pub fn tracing_err<'a, E: std::error::Error + 'static>(err: &'a E) -> impl tracing::Value + 'a {
    err as &dyn std::error::Error
}

pub(crate) fn tracing_duration(duration: Duration) -> impl tracing::Value {
    tracing::field::display(TracingDuration(duration))
}

struct TracingDuration(Duration);

impl fmt::Display for TracingDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.as_secs();
        if secs >= 60 {
            // Worker sleeps are measured in minutes and hours, sub-second
            // precision only adds noise there.
            return write!(f, "{}m {}s", secs / 60, secs % 60);
        }
        write!(f, "{:.2?}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use expect_test::expect;

    #[test]
    fn duration_formatting() {
        let test = |duration| TracingDuration(duration).to_string();

        expect!["1.50s"].assert_eq(&test(Duration::from_millis(1500)));
        expect!["5m 0s"].assert_eq(&test(Duration::from_secs(300)));
        expect!["61m 3s"].assert_eq(&test(Duration::from_secs(3663)));
    }
}
