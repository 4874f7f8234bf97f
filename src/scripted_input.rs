use ghostnet_core::MoveInput;
use ghostnet_net::ScriptedInput;
use serde::Deserialize;
use std::{fs, path::Path};

#[derive(Debug, Deserialize)]
struct ScriptedInputFile {
    steps: Vec<ScriptedStep>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct ScriptedStep {
    /// Ticks this step is held for.
    ticks: u32,
    #[serde(default)]
    horizontal: i32,
    #[serde(default)]
    vertical: i32,
}

/// Load a JSON script of `{ticks, horizontal, vertical}` steps.
pub fn load_script(path: &Path) -> anyhow::Result<ScriptedInput> {
    let contents = fs::read_to_string(path)?;
    parse_script(&contents)
}

fn parse_script(contents: &str) -> anyhow::Result<ScriptedInput> {
    let file: ScriptedInputFile = serde_json::from_str(contents)?;
    if file.steps.is_empty() {
        anyhow::bail!("scripted input file contains no steps");
    }
    let inputs = file.steps.into_iter().flat_map(|step| {
        let input = MoveInput {
            horizontal: step.horizontal.signum(),
            vertical: step.vertical.signum(),
        };
        std::iter::repeat(input).take(step.ticks as usize)
    });
    Ok(ScriptedInput::new(inputs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ghostnet_net::InputSource;

    #[test]
    fn steps_expand_per_tick() {
        let mut script = parse_script(
            r#"{"steps": [{"ticks": 2, "horizontal": 1}, {"ticks": 1, "vertical": -5}]}"#,
        )
        .unwrap();
        assert_eq!(script.remaining(), 3);

        let polled: Vec<_> = (0..4).map(|_| script.poll_input()).collect();
        assert_eq!(polled[0].horizontal, 1);
        assert_eq!(polled[1].horizontal, 1);
        assert_eq!(polled[2].vertical, -1);
        assert_eq!(polled[3], MoveInput::default());
    }

    #[test]
    fn empty_script_is_rejected() {
        assert!(parse_script(r#"{"steps": []}"#).is_err());
        assert!(parse_script("not json").is_err());
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.json");
        fs::write(&path, r#"{"steps": [{"ticks": 5}]}"#).unwrap();
        assert_eq!(load_script(&path).unwrap().remaining(), 5);
    }
}
