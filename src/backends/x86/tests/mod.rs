mod x86_test_support;

mod lowering_tests;
mod stack_effect_tests;
