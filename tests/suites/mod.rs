mod general;
mod mailbox;
mod rendezvous;
mod rescale;
