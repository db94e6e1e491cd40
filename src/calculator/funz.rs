//! Funz TCP protocol client: the line-oriented wire protocol spoken by a
//! running Funz calculator daemon.
//!
//! Grounded on `fz/runners.py::run_funz_calculation` and spec.md §6.3,
//! preserved bit-exact where compatibility matters — including the
//! `INTERUPT` method name, spelled as the original Java server spells it.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpStream, UdpSocket};
use std::time::Duration;

use crate::error::Error;
use crate::prelude::*;
use crate::value::ScalarValue;

pub struct FunzSession {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    secret: Option<String>,
}

/// One advertised calculator, from a UDP discovery broadcast.
#[derive(Debug, Clone)]
pub struct FunzAnnouncement {
    pub name: String,
    pub port: u16,
    pub secret: Option<String>,
    pub os: Option<String>,
    pub status: Option<String>,
}

pub fn discover(bind_port: u16, timeout: Duration) -> AppResult<Vec<FunzAnnouncement>> {
    let socket = UdpSocket::bind(("0.0.0.0", bind_port)).into_diagnostic().wrap_err("binding discovery socket")?;
    socket.set_read_timeout(Some(timeout)).into_diagnostic()?;

    let mut announcements = Vec::new();
    let mut buf = [0u8; 4096];

    loop {
        match socket.recv_from(&mut buf) {
            Ok((n, _addr)) => {
                let text = String::from_utf8_lossy(&buf[..n]);
                if let Some(announcement) = parse_announcement(&text) {
                    announcements.push(announcement);
                }
            }
            Err(_) => break,
        }
    }

    Ok(announcements)
}

fn parse_announcement(text: &str) -> Option<FunzAnnouncement> {
    let mut lines = text.lines();
    let name = lines.next()?.to_owned();
    let port: u16 = lines.next()?.trim().parse().ok()?;
    let secret = lines.next().map(str::to_owned);
    let os = lines.next().map(str::to_owned);
    let status = lines.next().map(str::to_owned);

    Some(FunzAnnouncement { name, port, secret, os, status })
}

impl FunzSession {
    pub fn connect(host: &str, port: u16, timeout: Duration) -> AppResult<Self> {
        let stream = TcpStream::connect((host, port))
            .into_diagnostic()
            .wrap_err_with(|| format!("connecting to funz calculator {host}:{port}"))?;
        stream.set_read_timeout(Some(timeout)).into_diagnostic()?;
        stream.set_write_timeout(Some(timeout)).into_diagnostic()?;

        let writer = stream.try_clone().into_diagnostic()?;
        Ok(FunzSession { reader: BufReader::new(stream), writer, secret: None })
    }

    fn send_line(&mut self, line: &str) -> AppResult<()> {
        writeln!(self.writer, "{line}").into_diagnostic().wrap_err("writing to funz session")
    }

    fn end_request(&mut self) -> AppResult<()> {
        self.send_line("/")
    }

    /// Reads lines until the `/` terminator, transparently discarding `H`
    /// heartbeats and consuming `I`-prefixed info messages (which occupy
    /// two lines: the `I` marker and the text itself).
    fn read_response_lines(&mut self) -> AppResult<Vec<String>> {
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            let n = self.reader.read_line(&mut line).into_diagnostic().wrap_err("reading funz response")?;
            if n == 0 {
                bail!("funz session closed unexpectedly");
            }
            let line = line.trim_end_matches(['\n', '\r']).to_owned();

            if line == "/" {
                return Ok(lines);
            }
            if line == "H" {
                continue;
            }
            if line == "I" {
                let mut info = String::new();
                self.reader.read_line(&mut info).into_diagnostic()?;
                continue;
            }
            lines.push(line);
        }
    }

    /// Splits the status first-line into its leading `Y`/`N`/`E` code and
    /// any space-separated fields on that same line (e.g. RESERVE's
    /// `Y secret ip security`), then appends whatever further lines the
    /// response carried (e.g. EXECUTE's trailing info lines).
    fn status_of(lines: &[String]) -> AppResult<(char, Vec<String>)> {
        let first = lines.first().ok_or_else(|| Error::FunzProtocolDesync {
            expected: "status line".to_owned(),
            got: "<empty response>".to_owned(),
        })?;
        let mut fields = first.split_whitespace();
        let status = fields
            .next()
            .and_then(|tok| tok.chars().next())
            .ok_or_else(|| Error::FunzProtocolDesync {
                expected: "Y/N/E".to_owned(),
                got: first.clone(),
            })?;
        let mut rest: Vec<String> = fields.map(str::to_owned).collect();
        rest.extend(lines[1..].iter().cloned());
        Ok((status, rest))
    }

    pub fn reserve(&mut self, project_code: &str, tagged: &[(String, ScalarValue)]) -> AppResult<()> {
        self.send_line("RESERVE")?;
        self.end_request()?;
        let lines = self.read_response_lines()?;
        let (status, _) = Self::status_of(&lines)?;
        if status != 'Y' {
            bail!("RESERVE phase 1 rejected: {:?}", lines);
        }

        self.send_line(project_code)?;
        self.send_line(&tagged.len().to_string())?;
        for (key, value) in tagged {
            self.send_line(key)?;
            self.send_line(&value.to_string())?;
        }
        self.end_request()?;

        let lines = self.read_response_lines()?;
        let (status, rest) = Self::status_of(&lines)?;
        if status != 'Y' {
            bail!("RESERVE phase 2 rejected: {:?}", lines);
        }
        self.secret = rest.first().cloned();
        Ok(())
    }

    pub fn newcase(&mut self, variables: &[(String, ScalarValue)]) -> AppResult<()> {
        self.send_line("NEWCASE")?;
        self.send_line(&variables.len().to_string())?;
        for (key, value) in variables {
            self.send_line(key)?;
            let rendered = value.to_string();
            let first_line = rendered.lines().next().unwrap_or_default();
            if rendered.contains('\n') {
                self.send_line(&format!("{first_line}..."))?;
            } else {
                self.send_line(&rendered)?;
            }
        }
        self.end_request()?;

        let lines = self.read_response_lines()?;
        let (status, _) = Self::status_of(&lines)?;
        if status != 'Y' {
            bail!("NEWCASE rejected: {:?}", lines);
        }
        Ok(())
    }

    pub fn putfile(&mut self, name: &str, contents: &[u8]) -> AppResult<()> {
        self.send_line(&format!("PUTFILE {name} {}", contents.len()))?;
        self.end_request()?;

        let lines = self.read_response_lines()?;
        let (status, _) = Self::status_of(&lines)?;
        if status != 'Y' {
            bail!("PUTFILE rejected for {name}: {:?}", lines);
        }

        self.writer.write_all(contents).into_diagnostic().wrap_err("writing file bytes")?;
        Ok(())
    }

    pub fn execute(&mut self, code: &str) -> AppResult<Vec<String>> {
        self.send_line(&format!("EXECUTE {code}"))?;
        self.end_request()?;
        let lines = self.read_response_lines()?;
        let (status, rest) = Self::status_of(&lines)?;
        if status == 'E' {
            bail!("EXECUTE failed: {:?}", rest);
        }
        Ok(rest)
    }

    pub fn archive(&mut self) -> AppResult<()> {
        self.send_line("ARCHIVE")?;
        self.end_request()?;
        let lines = self.read_response_lines()?;
        let (status, _) = Self::status_of(&lines)?;
        if status != 'Y' {
            bail!("ARCHIVE rejected: {:?}", lines);
        }
        Ok(())
    }

    /// Returns the raw zip bytes of the results archive.
    pub fn getfile(&mut self) -> AppResult<Vec<u8>> {
        self.send_line("GETFILE")?;
        self.end_request()?;

        let lines = self.read_response_lines()?;
        let (status, _) = Self::status_of(&lines)?;
        if status != 'Y' {
            bail!("GETFILE rejected: {:?}", lines);
        }

        self.send_line("ACK")?;

        let mut size_line = String::new();
        self.reader.read_line(&mut size_line).into_diagnostic()?;
        let size: usize = size_line.trim().parse().map_err(|_| Error::FunzProtocolDesync {
            expected: "decimal size".to_owned(),
            got: size_line.trim().to_owned(),
        })?;

        let mut buf = vec![0u8; size];
        self.reader.read_exact(&mut buf).into_diagnostic().wrap_err("reading archive bytes")?;
        Ok(buf)
    }

    pub fn unreserve(&mut self) -> AppResult<()> {
        let secret = self.secret.clone().unwrap_or_default();
        self.send_line(&format!("UNRESERVE {secret}"))?;
        let _ = self.end_request();
        let _ = self.read_response_lines();
        Ok(())
    }

    /// Spelled `INTERUPT` to match the legacy Java server's method name.
    pub fn interrupt(&mut self) -> AppResult<()> {
        let secret = self.secret.clone().unwrap_or_default();
        self.send_line(&format!("INTERUPT {secret}"))?;
        let _ = self.end_request();
        let _ = self.read_response_lines();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_announcement() {
        let text = "calc-01\n9090\nsecretvalue\nlinux\nidle\n";
        let announcement = parse_announcement(text).unwrap();
        assert_eq!(announcement.name, "calc-01");
        assert_eq!(announcement.port, 9090);
        assert_eq!(announcement.secret.as_deref(), Some("secretvalue"));
    }

    #[test]
    fn status_extraction_splits_first_line() {
        let lines = vec!["Y somesecret 10.0.0.1 med".to_owned()];
        let (status, rest) = FunzSession::status_of(&lines).unwrap();
        assert_eq!(status, 'Y');
        assert_eq!(rest, vec!["somesecret", "10.0.0.1", "med"]);
    }
}
