use super::action::ActionId;

/// Highest step index in a run. Indices are written with four digits, so
/// up to here file names sort in step order.
pub const MAX_STEPS: u32 = 9999;

/// Kind of a numbered file in a run directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepKind {
    User,
    Plan,
    Command(ActionId),
    Result(ActionId),
    Stream(ActionId),
    Warn,
    /// System-level failure of a turn (e.g. the backend returned nothing).
    Error,
}

impl StepKind {
    /// File name for this step at `index`: `0003_COMMAND__r1.md`,
    /// `0005_STREAM__r1.stdout.log`.
    pub fn file_name(&self, index: u32) -> String {
        match self {
            StepKind::User => format!("{index:04}_USER.md"),
            StepKind::Plan => format!("{index:04}_PLAN.md"),
            StepKind::Command(id) => format!("{index:04}_COMMAND__{id}.md"),
            StepKind::Result(id) => format!("{index:04}_RESULT__{id}.md"),
            StepKind::Stream(id) => format!("{index:04}_STREAM__{id}.stdout.log"),
            StepKind::Warn => format!("{index:04}_WARN.md"),
            StepKind::Error => format!("{index:04}_ERROR.md"),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            StepKind::User => "USER",
            StepKind::Plan => "PLAN",
            StepKind::Command(_) => "COMMAND",
            StepKind::Result(_) => "RESULT",
            StepKind::Stream(_) => "STREAM",
            StepKind::Warn => "WARN",
            StepKind::Error => "ERROR",
        }
    }

    pub fn action_id(&self) -> Option<&ActionId> {
        match self {
            StepKind::Command(id) | StepKind::Result(id) | StepKind::Stream(id) => Some(id),
            _ => None,
        }
    }

    /// Inverse of [`StepKind::file_name`].
    pub fn parse_file_name(name: &str) -> Option<(u32, StepKind)> {
        let (index, rest) = name.split_once('_')?;
        if index.len() < 4 || !index.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let index: u32 = index.parse().ok()?;

        let kind = if let Some(id) = rest.strip_prefix("STREAM__") {
            StepKind::Stream(ActionId::parse(id.strip_suffix(".stdout.log")?).ok()?)
        } else {
            let stem = rest.strip_suffix(".md")?;
            match stem {
                "USER" => StepKind::User,
                "PLAN" => StepKind::Plan,
                "WARN" => StepKind::Warn,
                "ERROR" => StepKind::Error,
                _ => {
                    let (label, id) = stem.split_once("__")?;
                    let id = ActionId::parse(id).ok()?;
                    match label {
                        "COMMAND" => StepKind::Command(id),
                        "RESULT" => StepKind::Result(id),
                        _ => return None,
                    }
                }
            }
        };
        Some((index, kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ActionId {
        ActionId::parse(s).unwrap()
    }

    #[test]
    fn test_file_names_match_layout() {
        assert_eq!(StepKind::User.file_name(1), "0001_USER.md");
        assert_eq!(StepKind::Plan.file_name(2), "0002_PLAN.md");
        assert_eq!(StepKind::Command(id("r1")).file_name(3), "0003_COMMAND__r1.md");
        assert_eq!(StepKind::Result(id("r1")).file_name(4), "0004_RESULT__r1.md");
        assert_eq!(
            StepKind::Stream(id("r1")).file_name(5),
            "0005_STREAM__r1.stdout.log"
        );
        assert_eq!(StepKind::Warn.file_name(6), "0006_WARN.md");
        assert_eq!(
            StepKind::Warn.file_name(MAX_STEPS),
            format!("{MAX_STEPS}_WARN.md")
        );
    }

    #[test]
    fn test_parse_file_name() {
        for (i, kind) in [
            StepKind::User,
            StepKind::Plan,
            StepKind::Command(id("step__x")),
            StepKind::Result(id("r1")),
            StepKind::Stream(id("r.1")),
            StepKind::Warn,
            StepKind::Error,
        ]
        .into_iter()
        .enumerate()
        {
            let name = kind.file_name(i as u32 + 1);
            assert_eq!(
                StepKind::parse_file_name(&name),
                Some((i as u32 + 1, kind))
            );
        }
        assert_eq!(StepKind::parse_file_name("index.md"), None);
        assert_eq!(StepKind::parse_file_name("env.json"), None);
        assert_eq!(StepKind::parse_file_name("0001_OTHER.md"), None);
    }
}
