//! Line-delimited JSON spoken with the trainer worker.
//!
//! Each request is one JSON object on the worker's stdin, tagged by `op`.
//! The worker answers with any number of `saved` notices followed by exactly
//! one terminal `ok` or `error`, each on its own stdout line.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use stylegan2_config::{LoadFrom, TrainerArgs};

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request<'a> {
    Init {
        args: &'a TrainerArgs,
    },
    InitProcessGroup {
        backend: &'a str,
        rank: usize,
        world_size: usize,
        seed: u64,
    },
    DestroyProcessGroup,
    Load {
        from: LoadFrom,
    },
    Clear,
    SetDataSrc {
        path: &'a str,
    },
    Train,
    Save {
        num: u64,
    },
    Evaluate {
        name: &'a str,
        num_image_tiles: usize,
    },
    GenerateInterpolation {
        name: &'a str,
        num_image_tiles: usize,
        num_steps: usize,
        save_frames: bool,
    },
    PrintLog,
    Shutdown,
}

impl Request<'_> {
    /// Operation name, for logs and errors.
    #[must_use]
    pub fn op(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::InitProcessGroup { .. } => "init_process_group",
            Self::DestroyProcessGroup => "destroy_process_group",
            Self::Load { .. } => "load",
            Self::Clear => "clear",
            Self::SetDataSrc { .. } => "set_data_src",
            Self::Train => "train",
            Self::Save { .. } => "save",
            Self::Evaluate { .. } => "evaluate",
            Self::GenerateInterpolation { .. } => "generate_interpolation",
            Self::PrintLog => "print_log",
            Self::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Terminal success, carrying the trainer's counters after the call.
    Ok {
        steps: u64,
        checkpoint_num: u64,
        #[serde(default)]
        message: Option<String>,
    },
    /// The trainer wrote a checkpoint.
    Saved { path: PathBuf },
    /// Terminal failure.
    Error {
        #[serde(default)]
        kind: ErrorKind,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Numerical instability; the step may be retried.
    Nan,
    #[default]
    #[serde(other)]
    Other,
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use stylegan2_config::TrainParams;

    use super::*;

    #[test]
    fn test_request_encoding() {
        let req = Request::Evaluate {
            name: "faces-0",
            num_image_tiles: 8,
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"op": "evaluate", "name": "faces-0", "num_image_tiles": 8})
        );
        assert_eq!(req.op(), "evaluate");

        assert_eq!(
            serde_json::to_value(Request::Load {
                from: LoadFrom::Latest
            })
            .unwrap(),
            json!({"op": "load", "from": -1})
        );
        assert_eq!(
            serde_json::to_value(Request::Train).unwrap(),
            json!({"op": "train"})
        );
    }

    #[test]
    fn test_init_carries_trainer_args() {
        let args = TrainerArgs::single(&TrainParams::default());
        let value = serde_json::to_value(Request::Init { args: &args }).unwrap();
        assert_eq!(value["op"], "init");
        assert_eq!(value["args"]["lr"], json!(2e-4));
        assert_eq!(value["args"]["is_ddp"], json!(false));
    }

    #[test]
    fn test_response_decoding() {
        let ok: Response =
            serde_json::from_str(r#"{"type":"ok","steps":12,"checkpoint_num":3}"#).unwrap();
        assert_eq!(
            ok,
            Response::Ok {
                steps: 12,
                checkpoint_num: 3,
                message: None
            }
        );

        let saved: Response =
            serde_json::from_str(r#"{"type":"saved","path":"models/faces/model_3.pt"}"#).unwrap();
        assert_eq!(
            saved,
            Response::Saved {
                path: PathBuf::from("models/faces/model_3.pt")
            }
        );

        let nan: Response =
            serde_json::from_str(r#"{"type":"error","kind":"nan","message":"NaN detected"}"#)
                .unwrap();
        assert!(matches!(
            nan,
            Response::Error {
                kind: ErrorKind::Nan,
                ..
            }
        ));

        let other: Response =
            serde_json::from_str(r#"{"type":"error","kind":"cuda_oom","message":"oom"}"#).unwrap();
        assert!(matches!(
            other,
            Response::Error {
                kind: ErrorKind::Other,
                ..
            }
        ));
    }
}
