use crate::common_io::Delimiter;

/// Read and write dense numeric matrices from and to files
pub trait IoOps {
    type Scalar;
    type Mat;

    /// Read a purely numeric table.
    ///
    /// * `file` - file name--either gzipped or not
    /// * `delim` - column separator
    /// * `skip` - index of a header line to drop (`None` = no header)
    fn read_file_delim(
        file: &str,
        delim: impl Into<Delimiter>,
        skip: Option<usize>,
    ) -> anyhow::Result<Self::Mat>;

    /// Write values in scientific notation with `digits` decimals
    fn write_file_delim(&self, file: &str, delim: &str, digits: usize) -> anyhow::Result<()>;
}

/// Pairwise distances between the rows of matrices
pub trait DistanceOps {
    type Scalar;
    type Mat;

    /// `D[i,j] = || self[i,:] - self[j,:] ||`; symmetric with an exact zero diagonal
    fn pairwise_euclidean_rows(&self) -> Self::Mat;

    /// `D[i,j] = || self[i,:] - other[j,:] ||`
    fn cross_euclidean_rows(&self, other: &Self::Mat) -> anyhow::Result<Self::Mat>;

    /// `D[i,j] = 1 - pearson(self[i,:], other[j,:])`; rows without
    /// variance are treated as uncorrelated with everything else
    fn pairwise_correlation_distance_rows(&self) -> Self::Mat;
}

/// Column-wise scaling
pub trait MatOps {
    type Mat;
    type Scalar;

    /// Divide every column by its own maximum; all-zero columns stay zero
    fn scale_columns_by_max(&self) -> Self::Mat;

    fn scale_columns_by_max_inplace(&mut self);

    /// The largest finite entry, if any
    fn max_finite(&self) -> Option<Self::Scalar>;
}
