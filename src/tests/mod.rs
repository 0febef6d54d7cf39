mod arena_selftest;
