pub mod content_router;
