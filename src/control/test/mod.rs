mod dbus_server_test;
