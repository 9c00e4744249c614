mod poller_tests;
mod session_tests;
