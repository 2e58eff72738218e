mod controller_response;
mod cycler_cadence;
mod fsm_path;
mod moving_average;
mod plc_jobs;
mod runtime_setup;
