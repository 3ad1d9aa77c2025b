use crate::common_io::{open_buf_writer, read_lines_of_words_generic, Delimiter};
use crate::traits::IoOps;
use ndarray::prelude::*;
use std::fmt::{Debug, LowerExp};
use std::io::Write;
use std::str::FromStr;

impl<T> IoOps for Array2<T>
where
    T: FromStr + Send + LowerExp + Clone,
    <T as FromStr>::Err: Debug,
{
    type Scalar = T;
    type Mat = Self;

    fn read_file_delim(
        file: &str,
        delim: impl Into<Delimiter>,
        skip: Option<usize>,
    ) -> anyhow::Result<Self::Mat> {
        let out = read_lines_of_words_generic(file, delim, skip, |w| {
            w.parse::<T>()
                .map_err(|e| anyhow::anyhow!("not a number: {:?}", e))
        })?;
        rows_to_array(out.lines, file)
    }

    fn write_file_delim(&self, file: &str, delim: &str, digits: usize) -> anyhow::Result<()> {
        let mut buf = open_buf_writer(file)?;
        for row in self.rows() {
            let line = row
                .iter()
                .map(|x| format!("{:.*e}", digits, x))
                .collect::<Vec<_>>()
                .join(delim);
            writeln!(buf, "{}", line)?;
        }
        buf.flush()?;
        Ok(())
    }
}

fn rows_to_array<T>(rows: Vec<Vec<T>>, file: &str) -> anyhow::Result<Array2<T>> {
    if rows.is_empty() {
        return Err(anyhow::anyhow!("no data in file {}", file));
    }
    let ncols = rows[0].len();
    if let Some((i, r)) = rows.iter().enumerate().find(|(_, r)| r.len() != ncols) {
        return Err(anyhow::anyhow!(
            "{}: data row {} has {} fields, expected {}",
            file,
            i + 1,
            r.len(),
            ncols
        ));
    }
    let nrows = rows.len();
    let data = rows.into_iter().flatten().collect::<Vec<_>>();
    Ok(Array2::from_shape_vec((nrows, ncols), data)?)
}

/// A numeric table with names along the rows and/or columns
pub struct NamedTable {
    pub row_names: Vec<Box<str>>,
    pub col_names: Vec<Box<str>>,
    pub data: Array2<f64>,
}

///
/// Read a whitespace-delimited table whose first line is a header of
/// column names.
///
/// * `file` - file name--either gzipped or not
/// * `has_row_names` - the first field of every data line is a name;
///   a header with one extra leading label is accepted
///
pub fn read_named_table(file: &str, has_row_names: bool) -> anyhow::Result<NamedTable> {
    let out = read_lines_of_words_generic(file, Delimiter::Whitespace, Some(0), |w| {
        Ok(w.to_owned().into_boxed_str())
    })?;

    let mut row_names = vec![];
    let mut rows = Vec::with_capacity(out.lines.len());
    for (i, words) in out.lines.into_iter().enumerate() {
        let mut words = words.into_iter();
        if has_row_names {
            let name = words
                .next()
                .ok_or_else(|| anyhow::anyhow!("{}: empty data row {}", file, i + 1))?;
            row_names.push(name);
        }
        let values = words
            .map(|w| {
                w.parse::<f64>().map_err(|_| {
                    anyhow::anyhow!("{}: data row {}, `{}` is not a number", file, i + 1, w)
                })
            })
            .collect::<anyhow::Result<Vec<f64>>>()?;
        rows.push(values);
    }

    let data = rows_to_array(rows, file)?;

    let mut col_names = out.header;
    if col_names.len() == data.ncols() + 1 && has_row_names {
        col_names.remove(0);
    }
    if col_names.len() != data.ncols() {
        return Err(anyhow::anyhow!(
            "{}: header has {} names for {} data columns",
            file,
            col_names.len(),
            data.ncols()
        ));
    }

    Ok(NamedTable {
        row_names,
        col_names,
        data,
    })
}
