//! Line-oriented command language that drives a `FlatFs` session.
//!
//! ```text
//! M <disk>          mount           C <name> <size>   create
//! D <name>          delete          R <name> <block>  read into buffer
//! W <name> <block>  write buffer    B <bytes...>      fill buffer
//! L                 list            E <name> <size>   resize
//! O                 defragment      Y <name>          change directory
//! ```

use std::io::{self, BufRead, Write};

use log::debug;

use crate::fs::{FlatFs, FsError};
use crate::layout::{FLATFS_BLOCK_SIZE, FLATFS_NAME_LEN};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Mount(String),
    Create(String, i64),
    Delete(String),
    Read(String, i64),
    Write(String, i64),
    Buffer(Vec<u8>),
    List,
    Resize(String, i64),
    Defragment,
    ChangeDirectory(String),
}

impl Command {
    /// `None` for anything malformed: unknown letter, wrong arity, bad number,
    /// or a name over five bytes.
    pub fn parse(line: &str) -> Option<Command> {
        let mut tokens = line.split(' ').filter(|t| !t.is_empty());
        let op = tokens.next()?;

        if op == "B" {
            // everything after "B " is payload, spaces included
            let rest = line.trim_start_matches(' ').strip_prefix("B ")?;
            if rest.is_empty() {
                return None;
            }
            let payload = &rest.as_bytes()[..rest.len().min(FLATFS_BLOCK_SIZE)];
            return Some(Command::Buffer(payload.to_vec()));
        }

        let args: Vec<&str> = tokens.collect();
        let cmd = match (op, args.as_slice()) {
            ("M", [disk]) => Command::Mount(disk.to_string()),
            ("C", [name, size]) => Command::Create(name_arg(name)?, number(size)?),
            ("D", [name]) => Command::Delete(name_arg(name)?),
            ("R", [name, block]) => Command::Read(name_arg(name)?, number(block)?),
            ("W", [name, block]) => Command::Write(name_arg(name)?, number(block)?),
            ("L", []) => Command::List,
            ("E", [name, size]) => Command::Resize(name_arg(name)?, number(size)?),
            ("O", []) => Command::Defragment,
            ("Y", [name]) => Command::ChangeDirectory(name_arg(name)?),
            _ => return None,
        };
        Some(cmd)
    }
}

fn name_arg(s: &str) -> Option<String> {
    (s.len() <= FLATFS_NAME_LEN).then(|| s.to_string())
}

fn number(s: &str) -> Option<i64> {
    s.parse().ok()
}

/// Runs one parsed command; listings go to `out`.
pub fn execute<W: Write>(
    fs: &mut FlatFs,
    cmd: &Command,
    out: &mut W,
) -> io::Result<Result<(), FsError>> {
    let result = match cmd {
        Command::Mount(disk) => fs.mount(disk),
        Command::Create(name, size) => fs.create(name, *size),
        Command::Delete(name) => fs.delete(name),
        Command::Read(name, block) => fs.read(name, *block),
        Command::Write(name, block) => fs.write(name, *block),
        Command::Buffer(bytes) => fs.set_buffer(bytes),
        Command::List => match fs.list() {
            Ok(entries) => {
                for entry in entries {
                    writeln!(out, "{}", entry)?;
                }
                Ok(())
            }
            Err(e) => Err(e),
        },
        Command::Resize(name, size) => fs.resize(name, *size),
        Command::Defragment => fs.defragment(),
        Command::ChangeDirectory(name) => fs.change_directory(name),
    };
    Ok(result)
}

/// Feeds every line of `input` through the session. Malformed lines and
/// failed operations are reported on `err`; processing always continues.
/// The mounted volume, if any, is flushed and closed at the end.
pub fn run_script<R, W, E>(
    fs: &mut FlatFs,
    script_name: &str,
    input: R,
    out: &mut W,
    err: &mut E,
) -> io::Result<()>
where
    R: BufRead,
    W: Write,
    E: Write,
{
    for (idx, line) in input.lines().enumerate() {
        let line = line?;
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }

        let Some(cmd) = Command::parse(line) else {
            writeln!(err, "Command Error: {}, {}", script_name, idx + 1)?;
            continue;
        };

        if let Err(e) = execute(fs, &cmd, out)? {
            debug!("line {}: {:?} failed (errno {})", idx + 1, cmd, e.as_errno());
            writeln!(err, "Error: {}", e)?;
        }
    }

    if fs.is_mounted() {
        if let Err(e) = fs.unmount() {
            writeln!(err, "Error: {}", e)?;
        }
    }
    Ok(())
}
