pub mod typed_prometheus;
