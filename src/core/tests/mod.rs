mod component_tree_tests;
