//! Decodes a FLIF16 image file and writes the result as a raw,
//! interleaved pixel dump (8 or 16-bit big-endian samples, depending on
//! the stream's bit depth).

// CLI crates
extern crate clap;

extern crate env_logger;
extern crate flif16;

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use flif16::output::PixelBuffer;
use flif16::{DecodeStatus, Decoder};

use clap::{App, Arg};

// Reads the input file in chunks and feeds it to the decoder bit by
// bit, the way a streaming caller (network socket, pipe) would: the
// decoder itself never assumes the whole file is available at once.
const CHUNK_SIZE: usize = 64 * 1024;

fn decode_file(path: &Path) -> Result<Vec<PixelBuffer>, String> {
    let mut file = File::open(path).map_err(|e| format!("cannot open {:?}: {}", path, e))?;
    let mut decoder = Decoder::new();
    let mut chunk = vec![0u8; CHUNK_SIZE];
    let mut frames = Vec::new();

    loop {
        let n = file.read(&mut chunk).map_err(|e| format!("read error: {}", e))?;
        let input = if n == 0 { &[][..] } else { &chunk[..n] };
        loop {
            match decoder.decode(input) {
                Ok(DecodeStatus::Yield(buf)) => {
                    println!(
                        "frame decoded at {}x{} ({:?})",
                        buf.width, buf.height, buf.format
                    );
                    frames.push(buf);
                    // Keep draining queued frames before feeding more bytes.
                    continue;
                }
                Ok(DecodeStatus::NeedMoreInput) => break,
                Ok(DecodeStatus::EndOfStream) => return Ok(frames),
                Err(err) => return Err(format!("decode error: {}", err)),
            }
        }
        if n == 0 {
            // EOF reached but the decoder never reported EndOfStream.
            return Ok(frames);
        }
    }
}

fn write_frame<W: Write>(file: &mut BufWriter<W>, buf: &PixelBuffer) -> std::io::Result<()> {
    file.write_all(&buf.data)
}

fn main() -> std::io::Result<()> {
    env_logger::init();

    let matches = App::new("flif16-decode")
        .about("Decodes a FLIF16 image into a raw interleaved pixel dump")
        .arg(
            Arg::new("input-path")
                .help("FLIF16 file to decode")
                .short('i')
                .long("input")
                .takes_value(true)
                .required(true),
        )
        .arg(
            Arg::new("output-path")
                .help("Output file")
                .short('o')
                .long("output")
                .takes_value(true)
                .required(true),
        )
        .get_matches();

    let input_path = matches.value_of("input-path").map(Path::new).unwrap();
    let output_path = matches.value_of("output-path").map(Path::new).unwrap();

    let frames = decode_file(input_path).unwrap_or_else(|err| {
        eprintln!("{}", err);
        std::process::exit(1);
    });

    let mut output_file = BufWriter::new(File::create(output_path)?);
    for frame in &frames {
        write_frame(&mut output_file, frame)?;
    }

    println!("Done. {} frame(s) decoded.", frames.len());
    Ok(())
}
