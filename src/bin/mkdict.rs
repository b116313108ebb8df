//! Dictionary compiler: turns a `key<TAB>value` word list into a
//! double-array index file.
//!
//! Input lines may arrive in any order; they are staged through an ordered
//! map, so the builder always sees strictly ascending, deduplicated keys.
//! Pass `-` as the input file to read standard input.

use std::collections::BTreeMap;
use std::env;
use std::error::Error;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::process::ExitCode;

use libdat::DoubleArray;

fn read_pairs(reader: impl BufRead) -> Result<BTreeMap<Vec<u8>, i32>, Box<dyn Error>> {
    let mut dict = BTreeMap::new();
    for (line_id, line) in reader.lines().enumerate() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let (key, value) = line
            .split_once('\t')
            .ok_or_else(|| format!("line {}: expected key<TAB>value", line_id + 1))?;
        let value: i32 = value
            .trim()
            .parse()
            .map_err(|_| format!("line {}: bad value {:?}", line_id + 1, value))?;
        dict.insert(key.as_bytes().to_vec(), value);
    }
    Ok(dict)
}

/// One-line percent bar, redrawn in place and finished with a newline.
fn print_progress(prev_percent: &mut usize, done: usize, total: usize) {
    const BAR: &str = "******************************";
    let total = total.max(1);
    let percent = 100 * done / total;
    if *prev_percent == percent {
        return;
    }
    *prev_percent = percent;

    let filled = BAR.len() * done / total;
    print!(
        "building index: {percent:3}% |{:<width$}|\r",
        &BAR[..filled],
        width = BAR.len()
    );
    if percent >= 100 {
        println!();
    }
    let _ = io::stdout().flush();
}

fn run(input: &str, output: &str) -> Result<(), Box<dyn Error>> {
    let dict = if input == "-" {
        read_pairs(io::stdin().lock())?
    } else {
        read_pairs(BufReader::new(File::open(input)?))?
    };

    let keys: Vec<&[u8]> = dict.keys().map(|key| key.as_slice()).collect();
    let values: Vec<i32> = dict.values().copied().collect();

    let mut prev_percent = usize::MAX;
    let mut progress = |done: usize, total: usize| print_progress(&mut prev_percent, done, total);
    let da = DoubleArray::build(&keys, Some(&values), Some(&mut progress))?;
    da.save(output)?;

    println!("total words: {}", keys.len());
    println!("index size:  {} bytes", da.total_size());
    Ok(())
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    if args.len() != 3 {
        let name = args.first().map(String::as_str).unwrap_or("mkdict");
        eprintln!("usage: {name} wordsfile dictfile");
        eprintln!("build a double-array index from wordsfile (- for stdin)");
        return ExitCode::FAILURE;
    }

    match run(&args[1], &args[2]) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
