use std::{
    fs::File,
    io::{stdin, stdout, BufRead, BufReader, Write},
    path::Path,
};

use eyre::Result;

/// Allows for writing to File or Stdout depending on if a filename is
/// given.
pub fn stdout_or_file<P>(filename: Option<P>) -> Result<Box<dyn Write>>
where
    P: AsRef<Path>,
{
    if let Some(fp) = filename {
        let handle = File::create(fp)?;
        Ok(Box::new(handle))
    } else {
        let handle = stdout().lock();
        Ok(Box::new(handle))
    }
}

/// Buffered reading from File or Stdin depending on if a filename is
/// given.
pub fn stdin_or_file<P>(filename: Option<P>) -> Result<Box<dyn BufRead>>
where
    P: AsRef<Path>,
{
    if let Some(fp) = filename {
        let handle = BufReader::new(File::open(fp)?);
        Ok(Box::new(handle))
    } else {
        let handle = BufReader::new(stdin().lock());
        Ok(Box::new(handle))
    }
}
