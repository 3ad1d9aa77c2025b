pub mod common_io; // line-oriented text I/O, gzip aware
pub mod knn_graph; // exact kNN graphs and their geodesics
pub mod ndarray_io; // dense numeric tables
pub mod ndarray_util; // distances and column scaling on `Array2<f64>`
pub mod traits;
