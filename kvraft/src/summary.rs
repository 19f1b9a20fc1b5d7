/// Compact one-line representation of a value, for log lines that would otherwise dump a whole
/// message or entry list.
pub trait MessageSummary {
    fn summary(&self) -> String;
}

impl<T> MessageSummary for &[T]
where T: MessageSummary
{
    fn summary(&self) -> String {
        if self.is_empty() {
            return "{}".to_string();
        }

        if self.len() <= 5 {
            let res = self.iter().map(|x| x.summary()).collect::<Vec<_>>();
            return res.join(",");
        }

        match (self.first(), self.last()) {
            (Some(first), Some(last)) => format!("{} ... {}", first.summary(), last.summary()),
            _ => "{}".to_string(),
        }
    }
}

impl<T> MessageSummary for Vec<T>
where T: MessageSummary
{
    fn summary(&self) -> String {
        self.as_slice().summary()
    }
}

impl<T> MessageSummary for Option<T>
where T: MessageSummary
{
    fn summary(&self) -> String {
        match self {
            None => "None".to_string(),
            Some(x) => {
                format!("Some({})", x.summary())
            }
        }
    }
}
