//! worker 进程入口：从 stdin 读取任务，执行分析器，把结果写回 stdout

use std::io::{BufRead, Write};

use anyhow::{bail, Context, Result};
use tracing::{debug, warn};

use super::protocol::{encode_line, Handshake, Request, Response, WireOutcome};
use crate::analyser::AnalyserSet;

/// 在任意输入输出上运行 worker 循环，输入结束时返回
pub fn serve<R: BufRead, W: Write>(input: R, mut output: W) -> Result<()> {
    let mut lines = input.lines();

    let handshake = match lines.next() {
        Some(line) => line.context("failed to read worker handshake")?,
        None => bail!("worker input closed before handshake"),
    };
    let handshake: Handshake = serde_json::from_str(&handshake).context("invalid worker handshake")?;
    let analysers = AnalyserSet::from_specs(&handshake.analysers)?;

    debug!("Worker {} ready with {} analysers", std::process::id(), analysers.len());

    for line in lines {
        let line = line.context("failed to read worker request")?;
        if line.trim().is_empty() {
            continue;
        }

        let request: Request = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                warn!("Skipping malformed worker request: {}", err);
                continue;
            }
        };

        let outcome = match analysers.get(&request.category) {
            Some(analyser) => {
                match analyser.apply(&request.path, request.root.as_deref()) {
                    Ok(result) => WireOutcome::Completed {
                        data: result.map(|r| r.data),
                    },
                    Err(err) => WireOutcome::Failed {
                        message: format!("{:#}", err),
                    },
                }
            }
            None => WireOutcome::Failed {
                message: format!("unknown analyser category '{}'", request.category),
            },
        };

        let response = Response {
            job: request.job,
            outcome,
        };
        output.write_all(encode_line(&response)?.as_bytes())?;
        output.flush()?;
    }

    Ok(())
}

/// `deepscan worker` 子命令
pub fn serve_stdio() -> Result<()> {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    serve(stdin.lock(), stdout.lock())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyser::AnalyserSpec;
    use serde_json::Value;
    use std::fs;
    use std::io::Cursor;
    use tempfile::tempdir;

    #[test]
    fn test_serve_answers_each_request_in_order() {
        let temp_dir = tempdir().unwrap();
        let license = temp_dir.path().join("NOTICE");
        fs::write(&license, "SPDX-License-Identifier: MIT\n").unwrap();

        let handshake = Handshake {
            analysers: vec![AnalyserSpec::License { include_copyright: false, max_file_size: 1024 }],
        };
        let requests = [
            Request { job: 1, category: "license".to_string(), path: license.clone(), root: None },
            Request { job: 2, category: "nope".to_string(), path: license.clone(), root: None },
            Request {
                job: 3,
                category: "license".to_string(),
                path: temp_dir.path().join("missing"),
                root: None,
            },
        ];

        let mut input = encode_line(&handshake).unwrap();
        input.push_str("this is not json\n");
        for request in &requests {
            input.push_str(&encode_line(request).unwrap());
        }

        let mut output = Vec::new();
        serve(Cursor::new(input), &mut output).unwrap();

        let responses: Vec<Response> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(responses.len(), 3);
        assert_eq!(responses.iter().map(|r| r.job).collect::<Vec<_>>(), vec![1, 2, 3]);

        match &responses[0].outcome {
            WireOutcome::Completed { data: Some(data) } => assert_eq!(data["spdx"][0], Value::from("MIT")),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(matches!(&responses[1].outcome, WireOutcome::Failed { message } if message.contains("nope")));
        assert!(matches!(responses[2].outcome, WireOutcome::Failed { .. }));
    }

    #[test]
    fn test_serve_requires_handshake() {
        let mut output = Vec::new();
        assert!(serve(Cursor::new(""), &mut output).is_err());
        assert!(serve(Cursor::new("{}\n"), &mut output).is_err());
    }
}
