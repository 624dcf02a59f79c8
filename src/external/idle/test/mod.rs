mod x11_test;
