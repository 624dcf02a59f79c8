mod upower_test;
