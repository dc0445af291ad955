//! Interactive commands typed while the equalizer runs

use cascade_core::domain::control::SlotId;
use std::path::PathBuf;
use std::str::FromStr;

pub const HELP: &str = "\
commands:
  lp | hp | bp | bs | custom   toggle a filter slot
  on <slot> / off <slot>       set a filter slot explicitly
  cutoff <hz>                  custom lowpass cutoff (100-15000 Hz)
  gain <0..1>                  output gain
  capture                      start live capture
  play [file]                  play the loaded file, or load and play another
  stop                         stop capture or playback
  spectrum                     show the spectrum of the last block
  status                       show controls and source state
  presets                      list saved presets
  save <name> / load <name>    store or recall the current controls
  delete <name>                remove a saved preset
  export <in.wav> <out.wav>    render a file through the current controls
  help                         this text
  quit                         exit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Toggle(SlotId),
    Set(SlotId, bool),
    Cutoff(f32),
    Gain(f32),
    Capture,
    Play(Option<PathBuf>),
    Stop,
    Spectrum,
    Status,
    Presets,
    SavePreset(String),
    LoadPreset(String),
    DeletePreset(String),
    Export { input: PathBuf, output: PathBuf },
    Help,
    Quit,
}

fn number(arg: Option<&str>, what: &str) -> Result<f32, String> {
    let arg = arg.ok_or_else(|| format!("{what} needs a value"))?;
    arg.parse::<f32>()
        .ok()
        .filter(|x| x.is_finite())
        .ok_or_else(|| format!("'{arg}' is not a valid {what}"))
}

fn name(arg: Option<&str>, what: &str) -> Result<String, String> {
    arg.map(str::to_string)
        .ok_or_else(|| format!("{what} needs a name"))
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            return Err("empty command".to_string());
        };
        let arg = words.next();

        let command = match head.to_ascii_lowercase().as_str() {
            "on" | "off" => {
                let slot = arg.ok_or("which slot?")?.parse::<SlotId>()?;
                Command::Set(slot, head.eq_ignore_ascii_case("on"))
            }
            "cutoff" => Command::Cutoff(number(arg, "cutoff")?),
            "gain" => Command::Gain(number(arg, "gain")?),
            "capture" => Command::Capture,
            "play" => Command::Play(arg.map(PathBuf::from)),
            "stop" => Command::Stop,
            "spectrum" => Command::Spectrum,
            "status" => Command::Status,
            "presets" => Command::Presets,
            "save" => Command::SavePreset(name(arg, "save")?),
            "load" => Command::LoadPreset(name(arg, "load")?),
            "delete" | "rm" => Command::DeletePreset(name(arg, "delete")?),
            "export" => {
                let output = words.next();
                match (arg, output) {
                    (Some(input), Some(output)) => Command::Export {
                        input: PathBuf::from(input),
                        output: PathBuf::from(output),
                    },
                    _ => return Err("usage: export <in.wav> <out.wav>".to_string()),
                }
            }
            "help" | "?" => Command::Help,
            "quit" | "exit" | "q" => Command::Quit,
            other => Command::Toggle(
                other
                    .parse::<SlotId>()
                    .map_err(|_| format!("unknown command '{other}', try 'help'"))?,
            ),
        };
        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_toggles() {
        assert_eq!("lp".parse::<Command>().unwrap(), Command::Toggle(SlotId::Low));
        assert_eq!("BS".parse::<Command>().unwrap(), Command::Toggle(SlotId::BandStop));
        assert_eq!(
            "off custom".parse::<Command>().unwrap(),
            Command::Set(SlotId::Custom, false)
        );
    }

    #[test]
    fn test_values() {
        assert_eq!("cutoff 2000".parse::<Command>().unwrap(), Command::Cutoff(2000.0));
        assert_eq!("gain 0.5".parse::<Command>().unwrap(), Command::Gain(0.5));
        assert!("gain".parse::<Command>().is_err());
        assert!("cutoff loud".parse::<Command>().is_err());
        assert!("cutoff NaN".parse::<Command>().is_err());
    }

    #[test]
    fn test_sources_and_files() {
        assert_eq!("play".parse::<Command>().unwrap(), Command::Play(None));
        assert_eq!(
            "play song.wav".parse::<Command>().unwrap(),
            Command::Play(Some(PathBuf::from("song.wav")))
        );
        assert_eq!(
            "export a.wav b.wav".parse::<Command>().unwrap(),
            Command::Export {
                input: PathBuf::from("a.wav"),
                output: PathBuf::from("b.wav")
            }
        );
        assert!("export a.wav".parse::<Command>().is_err());
    }

    #[test]
    fn test_preset_commands() {
        assert_eq!(
            "save vocals".parse::<Command>().unwrap(),
            Command::SavePreset("vocals".to_string())
        );
        assert_eq!(
            "rm vocals".parse::<Command>().unwrap(),
            Command::DeletePreset("vocals".to_string())
        );
        assert!("delete".parse::<Command>().is_err());
    }

    #[test]
    fn test_unknown_and_empty() {
        assert!("".parse::<Command>().is_err());
        assert!("dance".parse::<Command>().is_err());
        assert_eq!("quit".parse::<Command>().unwrap(), Command::Quit);
    }
}
