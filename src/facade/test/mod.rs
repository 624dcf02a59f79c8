mod change_recorder;
mod facade_test;
