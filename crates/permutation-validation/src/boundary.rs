//! Boundary-scenario tests for the stepwise algorithms, collected in one
//! place rather than scattered across the modules they exercise.
