mod basis;
mod differential;
